use crate::{Kv, StoreError, StoreResult, io_error};
use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// Filesystem-backed key/value store: one file per key under
/// `<root>/kv`. Key characters outside `[A-Za-z0-9-_]` are percent-encoded
/// in the file name so arbitrary keys stay round-trippable.
#[derive(Clone)]
pub struct FsKv {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl fmt::Debug for FsKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsKv")
            .field("dir", &self.dir)
            .field("quota_bytes", &self.quota_bytes)
            .finish()
    }
}

impl FsKv {
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_quota(root, None)
    }

    pub fn open_with_quota(
        root: impl AsRef<Path>,
        quota_bytes: Option<usize>,
    ) -> StoreResult<Self> {
        let dir = root.as_ref().join("kv");
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir, quota_bytes })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }

    fn used_bytes(&self) -> StoreResult<usize> {
        let mut total = 0usize;
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.dir, e))?;
            let meta = entry.metadata().map_err(|e| io_error(entry.path(), e))?;
            if meta.is_file() {
                total += meta.len() as usize;
            }
        }
        Ok(total)
    }
}

impl Kv for FsKv {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(path, err)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        if let Some(capacity) = self.quota_bytes {
            let replaced = fs::metadata(&path).map(|m| m.len() as usize).unwrap_or(0);
            let needed = self.used_bytes()? - replaced + value.len();
            if needed > capacity {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed: needed - capacity,
                    capacity,
                });
            }
        }
        fs::write(&path, value).map_err(|e| io_error(path, e))
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(path, err)),
        }
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                keys.push(decode_key(name));
            }
        }
        Ok(keys)
    }
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if is_safe(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

fn decode_key(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = encoded.get(i + 1..i + 3)
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
