pub mod blog_post;
pub mod repair_request;
pub mod webhook_event;
