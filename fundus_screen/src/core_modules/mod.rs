pub mod dataset_index;
pub mod image_acceptance;
pub mod inference_client;
pub mod prediction;
pub mod subset_extractor;
pub mod utils;
