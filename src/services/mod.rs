pub mod profile_resolver;
