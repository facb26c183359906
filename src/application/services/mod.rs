pub mod bot_service;
