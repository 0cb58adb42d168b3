//! Small card-drawing application used by the crate's own tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fragcast_rt::tasks::timeout;

use crate::codec::{Attributes, Fragment};
use crate::dispatch::{Application, DispatchTable, Outcome, StateTag};
use crate::error::InvalidAction;
use crate::ids::SessionId;
use crate::outbox::ConnectionOutbox;
use crate::transport::{ChannelPeer, WireMessage};

pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub drawn: Vec<String>,
    pub turn: u32,
    pub over: bool,
}

/// Counts concurrent handler executions so tests can assert exclusivity.
#[derive(Debug, Default)]
pub struct Probe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Probe {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct Cards {
    pub probe: Arc<Probe>,
}

impl Application for Cards {
    type State = Table;

    fn state_tag(&self, state: &Table) -> StateTag {
        if state.over {
            "over"
        } else {
            "playing"
        }
    }

    fn dispatch_table(&self) -> DispatchTable<Table> {
        let probe = Arc::clone(&self.probe);
        DispatchTable::new()
            .on("playing", "draw_card", |table: &Table, attrs: &Attributes| {
                let player = attrs.require("player")?;
                let mut next = table.clone();
                next.drawn.push(player.to_string());
                Ok((next, Outcome::Continue))
            })
            .on("playing", "end_turn", |table: &Table, _: &Attributes| {
                let mut next = table.clone();
                next.turn += 1;
                Ok((next, Outcome::Continue))
            })
            .on("playing", "fold", |_: &Table, _: &Attributes| {
                Err(InvalidAction::rejected("folding is not allowed"))
            })
            .on("playing", "boom", |_: &Table, _: &Attributes| {
                panic!("handler blew up")
            })
            .on("playing", "finish", |table: &Table, _: &Attributes| {
                let mut next = table.clone();
                next.over = true;
                Ok((next, Outcome::End))
            })
            .on("playing", "slow", move |table: &Table, _: &Attributes| {
                let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_micros(200));
                probe.in_flight.fetch_sub(1, Ordering::SeqCst);
                let mut next = table.clone();
                next.turn += 1;
                Ok((next, Outcome::Continue))
            })
    }

    fn render(&self, session: &SessionId, table: &Table) -> Fragment {
        Fragment::new(format!(
            "<p>turn {}: {}</p>",
            table.turn,
            table.drawn.join(",")
        ))
        .with_meta(session.as_str())
    }
}

pub fn sid(raw: &str) -> SessionId {
    SessionId::new(raw).unwrap()
}

/// Waits for the next fragment on `outbox`, failing the test if none arrives.
pub async fn next_html(outbox: &mut ConnectionOutbox) -> String {
    timeout(WAIT, outbox.next())
        .await
        .expect("timed out waiting for a fragment")
        .expect("outbox closed")
        .html
}

/// Waits for the next message the server wrote to `peer`.
pub async fn next_wire(peer: &mut ChannelPeer) -> WireMessage {
    timeout(WAIT, peer.recv())
        .await
        .expect("timed out waiting for the server")
        .expect("server side dropped the transport")
}

pub fn text(html: &str, session: &str) -> WireMessage {
    WireMessage::Text(format!("{html}\n\n{session}"))
}
