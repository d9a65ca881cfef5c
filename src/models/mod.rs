pub mod jobmodel;
pub mod usermodel;
