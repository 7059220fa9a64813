pub mod detect_and_classify;
pub mod model_provider;
pub mod nearest_to_center;
