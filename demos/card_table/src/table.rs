//! Two-player card table.
//!
//! Players join by drawing. Once both seats are taken they alternate turns:
//! draw, play a card onto their score, or end the turn. The first player to
//! reach [`TARGET_SCORE`] wins and the session ends; conceding hands the win
//! to the other seat.

use fragcast_session::{
    Application, Attributes, DispatchTable, Fragment, HandlerResult, InvalidAction, Outcome,
    SessionId, StateTag,
};

pub const SEATS: usize = 2;
pub const HAND_LIMIT: usize = 5;
pub const TARGET_SCORE: u32 = 21;

const WAITING: StateTag = "waiting";
const PLAYING: StateTag = "playing";
const FINISHED: StateTag = "finished";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub name: String,
    pub hand: Vec<u8>,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState {
    pub players: Vec<Player>,
    /// Drawn from the back.
    pub deck: Vec<u8>,
    /// Index into `players` of whoever acts next.
    pub turn: usize,
    pub round: u32,
    pub winner: Option<String>,
}

impl Default for TableState {
    fn default() -> Self {
        Self {
            players: Vec::new(),
            deck: (0..40).map(|i| (i % 10 + 1) as u8).collect(),
            turn: 0,
            round: 1,
            winner: None,
        }
    }
}

impl TableState {
    fn seat_of(&self, name: &str) -> Option<usize> {
        self.players.iter().position(|p| p.name == name)
    }

    fn is_full(&self) -> bool {
        self.players.len() >= SEATS
    }

    fn advance_turn(&mut self) {
        self.turn = (self.turn + 1) % self.players.len().max(1);
        self.round += 1;
    }

    /// Seat of `name`, which must be the player whose turn it is.
    fn acting_seat(&self, name: &str) -> Result<usize, InvalidAction> {
        let seat = self
            .seat_of(name)
            .ok_or_else(|| InvalidAction::rejected(format!("{name} is not seated")))?;
        if seat != self.turn {
            return Err(InvalidAction::rejected(format!("not {name}'s turn")));
        }
        Ok(seat)
    }
}

fn draw_card(table: &TableState, attrs: &Attributes) -> HandlerResult<TableState> {
    let name = attrs.require("player")?;
    let mut next = table.clone();
    let seat = match next.seat_of(name) {
        Some(seat) => seat,
        None if next.is_full() => return Err(InvalidAction::rejected("table is full")),
        None => {
            next.players.push(Player {
                name: name.to_string(),
                hand: Vec::new(),
                score: 0,
            });
            next.players.len() - 1
        }
    };
    // Turns only count once both seats were already taken.
    if table.is_full() && seat != table.turn {
        return Err(InvalidAction::rejected(format!("not {name}'s turn")));
    }
    if next.players[seat].hand.len() >= HAND_LIMIT {
        return Err(InvalidAction::rejected("hand is full"));
    }
    let card = next
        .deck
        .pop()
        .ok_or_else(|| InvalidAction::rejected("deck is empty"))?;
    next.players[seat].hand.push(card);
    Ok((next, Outcome::Continue))
}

fn end_turn(table: &TableState, _: &Attributes) -> HandlerResult<TableState> {
    let mut next = table.clone();
    next.advance_turn();
    Ok((next, Outcome::Continue))
}

fn play_card(table: &TableState, attrs: &Attributes) -> HandlerResult<TableState> {
    let name = attrs.require("player")?;
    let card: u8 = attrs.parse("card")?;
    let seat = table.acting_seat(name)?;

    let mut next = table.clone();
    let player = &mut next.players[seat];
    let index = player
        .hand
        .iter()
        .position(|&c| c == card)
        .ok_or_else(|| InvalidAction::rejected(format!("{card} is not in {name}'s hand")))?;
    player.hand.remove(index);
    player.score += u32::from(card);

    if player.score >= TARGET_SCORE {
        next.winner = Some(name.to_string());
        return Ok((next, Outcome::End));
    }
    next.advance_turn();
    Ok((next, Outcome::Continue))
}

fn concede(table: &TableState, attrs: &Attributes) -> HandlerResult<TableState> {
    let name = attrs.require("player")?;
    let seat = table
        .seat_of(name)
        .ok_or_else(|| InvalidAction::rejected(format!("{name} is not seated")))?;
    let mut next = table.clone();
    next.winner = next
        .players
        .iter()
        .enumerate()
        .find(|(i, _)| *i != seat)
        .map(|(_, p)| p.name.clone());
    Ok((next, Outcome::End))
}

#[derive(Debug, Default)]
pub struct CardTable;

impl Application for CardTable {
    type State = TableState;

    fn state_tag(&self, table: &TableState) -> StateTag {
        if table.winner.is_some() {
            FINISHED
        } else if table.is_full() {
            PLAYING
        } else {
            WAITING
        }
    }

    fn dispatch_table(&self) -> DispatchTable<TableState> {
        DispatchTable::new()
            .on_each(&[WAITING, PLAYING], "draw_card", draw_card)
            .on_each(&[WAITING, PLAYING], "end_turn", end_turn)
            .on(PLAYING, "play_card", play_card)
            .on(PLAYING, "concede", concede)
    }

    fn render(&self, session: &SessionId, table: &TableState) -> Fragment {
        Fragment::new(render_table(session, table))
    }
}

pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_table(session: &SessionId, table: &TableState) -> String {
    let session = html_escape(session.as_str());
    let mut html = format!(
        "<section class=\"table\" data-session=\"{session}\">\
         <header>round {} &middot; {} cards left</header>\
         <div class=\"board\">",
        table.round,
        table.deck.len()
    );

    for (seat, player) in table.players.iter().enumerate() {
        let name = html_escape(&player.name);
        let acting = table.winner.is_none() && seat == table.turn;
        html.push_str(&format!(
            "<div class=\"hand\" data-player=\"{name}\" data-turn=\"{acting}\">\
             <h2>{name} <small>{}</small></h2>",
            player.score
        ));
        for card in &player.hand {
            html.push_str(&format!(
                "<button data-action=\"play_card\" data-player=\"{name}\" data-card=\"{card}\">{card}</button>"
            ));
        }
        html.push_str("</div>");
    }
    html.push_str("</div>");

    match &table.winner {
        Some(winner) => html.push_str(&format!(
            "<p class=\"winner\">{} wins</p>",
            html_escape(winner)
        )),
        None => html.push_str(
            "<footer>\
             <button data-action=\"draw_card\">draw</button>\
             <button data-action=\"end_turn\">end turn</button>\
             <button data-action=\"concede\">concede</button>\
             </footer>",
        ),
    }
    html.push_str("</section>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().copied().collect()
    }

    fn apply(table: &TableState, action: &str, pairs: &[(&str, &str)]) -> HandlerResult<TableState> {
        let app = CardTable;
        let dispatch = app.dispatch_table();
        let handler = dispatch
            .resolve(app.state_tag(table), action)
            .unwrap_or_else(|| panic!("no {action} handler for {}", app.state_tag(table)));
        handler(table, &attrs(pairs))
    }

    fn seated() -> TableState {
        let (table, _) = apply(&TableState::default(), "draw_card", &[("player", "p1")]).unwrap();
        let (table, _) = apply(&table, "draw_card", &[("player", "p2")]).unwrap();
        table
    }

    #[test]
    fn first_draw_seats_the_player() {
        let (table, outcome) =
            apply(&TableState::default(), "draw_card", &[("player", "p1")]).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(table.players.len(), 1);
        assert_eq!(table.players[0].hand, vec![10]);
        assert_eq!(table.deck.len(), 39);
        assert_eq!(CardTable.state_tag(&table), WAITING);
    }

    #[test]
    fn draw_requires_a_player() {
        assert_eq!(
            apply(&TableState::default(), "draw_card", &[]),
            Err(InvalidAction::MissingAttribute("player".to_string()))
        );
    }

    #[test]
    fn third_player_is_turned_away() {
        let table = seated();
        assert_eq!(CardTable.state_tag(&table), PLAYING);
        assert!(apply(&table, "draw_card", &[("player", "p3")]).is_err());
    }

    #[test]
    fn turns_are_enforced_once_seated() {
        let table = seated();
        assert!(apply(&table, "draw_card", &[("player", "p2")]).is_err());

        let (table, _) = apply(&table, "draw_card", &[("player", "p1")]).unwrap();
        let (table, _) = apply(&table, "end_turn", &[]).unwrap();
        assert_eq!(table.turn, 1);
        assert_eq!(table.round, 2);
        assert!(apply(&table, "draw_card", &[("player", "p2")]).is_ok());
    }

    #[test]
    fn end_turn_on_empty_table_still_advances_round() {
        let (table, _) = apply(&TableState::default(), "end_turn", &[]).unwrap();
        assert_eq!(table.turn, 0);
        assert_eq!(table.round, 2);
    }

    #[test]
    fn hand_limit_and_empty_deck_are_rejected() {
        let mut table = TableState::default();
        for _ in 0..HAND_LIMIT {
            table = apply(&table, "draw_card", &[("player", "p1")]).unwrap().0;
        }
        assert_eq!(
            apply(&table, "draw_card", &[("player", "p1")]),
            Err(InvalidAction::rejected("hand is full"))
        );

        let empty = TableState {
            deck: Vec::new(),
            ..TableState::default()
        };
        assert_eq!(
            apply(&empty, "draw_card", &[("player", "p1")]),
            Err(InvalidAction::rejected("deck is empty"))
        );
    }

    #[test]
    fn playing_to_target_ends_the_session() {
        let mut table = seated();
        table.players[0].hand = vec![10, 9];
        table.players[0].score = 12;

        let (table, outcome) =
            apply(&table, "play_card", &[("player", "p1"), ("card", "9")]).unwrap();
        assert_eq!(outcome, Outcome::End);
        assert_eq!(table.winner.as_deref(), Some("p1"));
        assert_eq!(table.players[0].hand, vec![10]);
        assert_eq!(CardTable.state_tag(&table), FINISHED);
        assert!(CardTable.dispatch_table().actions_for(FINISHED).is_empty());
    }

    #[test]
    fn play_card_validates_card_and_turn() {
        let table = seated();
        assert!(matches!(
            apply(&table, "play_card", &[("player", "p1"), ("card", "ace")]),
            Err(InvalidAction::InvalidAttribute { .. })
        ));
        assert!(apply(&table, "play_card", &[("player", "p1"), ("card", "3")]).is_err());
        assert!(apply(&table, "play_card", &[("player", "p2"), ("card", "9")]).is_err());

        let (next, outcome) =
            apply(&table, "play_card", &[("player", "p1"), ("card", "10")]).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(next.players[0].score, 10);
        assert_eq!(next.turn, 1);
    }

    #[test]
    fn concede_hands_win_to_opponent() {
        let (table, outcome) = apply(&seated(), "concede", &[("player", "p2")]).unwrap();
        assert_eq!(outcome, Outcome::End);
        assert_eq!(table.winner.as_deref(), Some("p1"));
    }

    #[test]
    fn render_escapes_player_names() {
        let session = SessionId::new("s<1>").unwrap();
        let (table, _) = apply(
            &TableState::default(),
            "draw_card",
            &[("player", "<script>alert(1)</script>")],
        )
        .unwrap();
        let html = CardTable.render(&session, &table).html;
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("data-session=\"s&lt;1&gt;\""));
        assert!(html.contains("data-action=\"draw_card\""));
    }
}
