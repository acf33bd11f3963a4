pub mod mock;

pub use mock::{BoardCall, MockBoard, MockRadio};
