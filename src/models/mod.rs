pub mod canarydrop;
pub mod token;
