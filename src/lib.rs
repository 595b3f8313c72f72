//! # chat2bear
//!
//! A CLI tool that moves [ChatGPT](https://chat.openai.com) conversations from a
//! data export into [Bear](https://bear.app), one note per conversation.
//!
//! ## What it does
//!
//! The export's `conversations.json` is read in full. Each conversation is
//! rendered into a note body (a link back to ChatGPT, then every turn with a role
//! marker; user turns fenced as code) and handed to Bear through its
//! `bear://x-callback-url/create` scheme. Bear reports success to a small local
//! listener, which is started for the duration of the run.
//!
//! ## The ledger
//!
//! A JSON-lines ledger maps conversation ids to Bear note ids. Conversations in
//! the ledger are skipped on later runs. A separate `check-exists` pass asks Bear
//! whether each recorded note still exists and rewrites the ledger with the
//! answers, one line per conversation.
//!
//! ## Usage
//!
//! ```sh
//! # Import up to 50 new conversations
//! chat2bear --export ~/Downloads/chatgpt/conversations.json --max 50
//!
//! # Re-check every recorded note
//! chat2bear --mode check-exists --force-check
//! ```
//!
//! Preferences can be persisted in `~/.config/chat2bear/config.toml`.
//!
//! ## Platform
//!
//! Bear is macOS-only and requests are delivered with `open -g`.

pub mod channel;
pub mod export;
pub mod ledger;
pub mod migrate;
pub mod reconcile;
pub mod renderer;
pub mod sanitize;
pub mod utils;
