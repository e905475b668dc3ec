//! Shared doubles for delivery tests
#![allow(dead_code)] // Not every test file uses every helper

use std::{
    collections::VecDeque,
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use courier_common::Message;
use courier_delivery::{Transport, TransportError};
use courier_maildir::{EntryRef, Maildir};

/// How the scripted transport answers one send
#[derive(Debug, Clone)]
pub enum Reply {
    Accept,
    Code(u16, &'static str),
    Disconnect,
}

/// A mail the transport was asked to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub sender: String,
    pub recipients: Vec<String>,
    pub data: Vec<u8>,
}

/// Transport that answers from a script and records every attempt.
///
/// Once the script runs out every send is accepted.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    attempts: Mutex<Vec<SentMail>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            attempts: Mutex::default(),
        })
    }

    /// Every send attempt, accepted or not
    pub fn attempts(&self) -> Vec<SentMail> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        sender: &str,
        recipients: &[String],
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.attempts.lock().unwrap().push(SentMail {
            sender: sender.to_string(),
            recipients: recipients.to_vec(),
            data: data.to_vec(),
        });

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Accept);

        match reply {
            Reply::Accept => Ok(()),
            Reply::Code(code, message) => Err(TransportError::Response {
                code,
                message: message.to_string(),
            }),
            Reply::Disconnect => Err(TransportError::Connection(
                "connection reset by peer".to_string(),
            )),
        }
    }
}

pub fn message(sender: &str, recipients: &[&str], body: &str) -> Message {
    Message::new(
        sender,
        recipients.iter().copied(),
        format!("Subject: {body}\r\n\r\n{body}\r\n").into_bytes(),
    )
}

pub async fn open_queue() -> (tempfile::TempDir, Maildir) {
    let dir = tempfile::tempdir().unwrap();
    let maildir = Maildir::open_path(dir.path().join("queue"), true)
        .await
        .unwrap();
    (dir, maildir)
}

/// Stage and publish `message` with its envelope embedded
pub async fn enqueue(maildir: &Maildir, message: &Message) -> EntryRef {
    let staged = maildir.stage_message(message).await.unwrap();
    staged.publish().await.unwrap();

    maildir
        .list_published()
        .await
        .unwrap()
        .into_iter()
        .find(|entry| &entry.name == staged.name())
        .unwrap()
}

pub fn set_age(path: &Path, age: Duration) {
    std::fs::File::options()
        .append(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

/// Names of everything in the published area, dot-files included
pub fn published_files(maildir: &Maildir) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(maildir.new_dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn staged_files(maildir: &Maildir) -> usize {
    std::fs::read_dir(maildir.tmp_dir()).unwrap().count()
}
