pub mod broker_client;

#[cfg(test)]
pub mod mock_broker;
