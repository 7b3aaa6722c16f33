pub mod batch;
pub mod catalog;
pub mod discount;
pub mod discount_rule;
pub mod quote;
pub mod tier;
