mod page;
mod table;

pub use page::pages;
pub use table::{CardTable, Player, TableState, HAND_LIMIT, SEATS, TARGET_SCORE};
