mod commands;
mod console;
mod helpers;
