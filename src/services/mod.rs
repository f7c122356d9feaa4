pub mod counting_api;
