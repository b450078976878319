pub mod checkpoint;
pub mod directory;
