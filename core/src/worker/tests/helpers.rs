//! Test helpers for session and server tests

use std::collections::VecDeque;

use crate::host::StandardHost;
use crate::interpreter::{compile, InterpreterConfig};
use crate::worker::{Command, Control, Event, Session, Status};

/// Control that hands out queued commands, one per poll, and records events.
/// A `None` entry is a poll with nothing waiting.
#[derive(Default)]
pub struct ScriptedControl {
    pub queued: VecDeque<Option<Command>>,
    pub events: Vec<Event>,
}

impl ScriptedControl {
    pub fn with_polls(polls: Vec<Option<Command>>) -> Self {
        Self {
            queued: polls.into(),
            events: Vec::new(),
        }
    }

    /// Events recorded so far, cleared
    pub fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Status(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_line(&self) -> Option<usize> {
        self.events.iter().rev().find_map(|e| match e {
            Event::Line(n) => Some(*n),
            _ => None,
        })
    }

    pub fn var_names(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Var(r) => Some(r.name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Control for ScriptedControl {
    fn poll(&mut self) -> Option<Command> {
        self.queued.pop_front().flatten()
    }

    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// Session over a compiled script, rooted in a fresh temp dir
pub fn session_for(source: &str) -> (Session, tempfile::TempDir) {
    let root = tempfile::tempdir().expect("temp dir");
    let program = compile(source, "session.ss").expect("Compile script failed");
    let host = StandardHost::new(root.path());
    let session = Session::new(program, Box::new(host), &InterpreterConfig::default())
        .expect("Session creation failed");
    (session, root)
}
