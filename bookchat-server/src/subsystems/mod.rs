pub mod generate;
pub mod retrieve;
