pub mod catalogue_controller;
pub mod health_controller;
pub mod stream_controller;
