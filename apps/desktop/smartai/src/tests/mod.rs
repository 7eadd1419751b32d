mod console;
mod error;
mod export;
