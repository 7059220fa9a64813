pub mod annotations;
pub mod classification;
pub mod config;
pub mod image_utils;
pub mod object_detection;
pub mod pipeline;
pub mod scan;
pub mod service;
