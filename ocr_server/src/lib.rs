pub mod detector;
pub mod engine;
pub mod recognizer;
pub mod service;

pub mod proto {
    tonic::include_proto!("ocr");
}
