pub mod ranking_table;
