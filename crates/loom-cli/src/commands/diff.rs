//! `loom diff`: structural comparison of two snapshot payloads.

use anyhow::Result;
use clap::Args;
use loom_snapshot::create_comparison;

use crate::input::parse_json_value;
use crate::opts::PageOpts;

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Old value: JSON literal, @file, or @- for stdin
    pub old: String,

    /// New value: JSON literal or @file
    pub new: String,
}

pub fn cmd_diff(opts: &PageOpts, args: &DiffArgs) -> Result<()> {
    let old = parse_json_value(&args.old)?;
    let new = parse_json_value(&args.new)?;
    opts.print(&create_comparison(&old, &new))
}
