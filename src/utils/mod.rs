pub mod currency;
pub mod reference;
pub mod token;
