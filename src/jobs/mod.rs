pub mod daily_pipeline;
