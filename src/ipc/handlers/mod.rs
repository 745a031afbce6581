pub mod classes;
pub mod core;
pub mod grade_import;
pub mod students;
