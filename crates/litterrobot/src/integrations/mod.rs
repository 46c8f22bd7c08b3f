pub mod litterrobot;
