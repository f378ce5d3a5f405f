pub mod todo;

pub use todo::{Attachment, NewTodo, QueryEmission, Todo, TodoWithImageUrl};
