pub mod autotrader;
pub mod circuit_breaker;
pub mod discovery;
pub mod executor;
pub mod exit;
pub mod monitor;
pub mod position;
pub mod validator;

#[cfg(test)]
pub mod test_support;

