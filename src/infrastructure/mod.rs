pub mod alpaca_client;
