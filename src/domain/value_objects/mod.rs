pub mod identifier;
pub mod price;
pub mod quantity;
