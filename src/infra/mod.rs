pub mod telraam;
