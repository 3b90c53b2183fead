pub mod descs;
pub mod handle_table;
pub mod records;
pub mod resource_tables;
pub mod transient_allocator;
