pub mod backup;
pub mod diff;
pub mod images;
pub mod lock;
pub mod recover;
pub mod run;
