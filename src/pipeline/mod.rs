pub mod export;
pub mod pattern;
pub mod persistence;
pub mod project;
pub mod render;
pub mod song;
