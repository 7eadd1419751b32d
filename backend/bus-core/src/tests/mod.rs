mod health;
mod message;
mod pending;
mod retry;
mod state;
mod transport;
