mod config;
mod session_http;
mod store_outage;
