pub mod blocks;
pub mod filters;
pub mod links;
pub mod mentions;
pub mod time_window;
