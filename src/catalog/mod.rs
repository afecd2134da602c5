pub mod def;
pub mod fs;
pub mod mgr;
pub mod path;
