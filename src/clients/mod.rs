pub mod retail_prices;
