pub mod api;
pub mod config;
pub mod orm;
pub mod routes;
pub mod url_repo;
pub mod url_service;
