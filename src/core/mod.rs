pub mod storage;
pub mod tensor;
pub mod types;
