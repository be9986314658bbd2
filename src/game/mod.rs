pub mod leaderboard;
pub mod qualify;
pub mod ranking;
pub mod submission;
