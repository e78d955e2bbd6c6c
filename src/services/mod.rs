pub mod collection;
pub mod joining;
pub mod normalize;
pub mod retention;
