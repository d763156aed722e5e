pub mod ascii_preview;

pub use ascii_preview::{AsciiRenderer, clear_screen};
