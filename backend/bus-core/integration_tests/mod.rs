mod bus_tests;
mod helpers;
mod orchestrator;
mod supervision;
mod transport;
