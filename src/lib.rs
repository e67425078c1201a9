pub mod capture;
pub mod core;
pub mod playlist;
pub mod segments;
pub mod shared;
pub mod web;
