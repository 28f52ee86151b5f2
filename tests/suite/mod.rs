mod log;
mod remote;
mod scheduling;
