pub mod profile_client;
