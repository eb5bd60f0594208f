//! API handlers module

pub mod clippings;
pub mod form;
pub mod health;
pub mod pages;
pub mod papers;
