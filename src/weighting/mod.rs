pub mod covariance;
pub mod schemes;

pub use covariance::{
    ledoit_wolf, predicted_tracking_error, returns_from_prices, sample_covariance,
    CovarianceMethod,
};
pub use schemes::{
    equal_weights, inverse_volatility, limit_weights, mean_variance, random_weights, risk_parity,
    RiskParityMethod,
};
