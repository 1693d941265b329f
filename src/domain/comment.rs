use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::attachment::Attachment;
use crate::domain::moderation::Moderatable;
use crate::domain::user::AuthorSummary;

/// A comment as stored: flat, with an optional parent reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub author: AuthorSummary,
    #[serde(skip)]
    pub author_active: bool,
    pub parent_comment_id: Option<Uuid>,
    pub content: String,
    /// Users who liked the comment; each appears once.
    #[serde(skip)]
    pub likes: Vec<Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Moderatable for Comment {
    const TABLE: &'static str = "comments";
    const TARGET_TYPE: &'static str = "comment";

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }
}

/// A comment as returned to clients, with its direct replies nested.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommentNode {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub author: AuthorSummary,
    pub parent_comment_id: Option<Uuid>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub is_active: bool,
    pub like_count: usize,
    /// Whether the requesting user liked this comment. Always false for
    /// anonymous requests.
    pub liked: bool,
    /// Number of direct replies, not the size of the whole subtree.
    pub reply_count: usize,
    pub replies: Vec<CommentNode>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CommentNode {
    pub fn from_comment(comment: Comment, requester_id: Option<Uuid>) -> Self {
        let liked = requester_id.map_or(false, |id| comment.likes.contains(&id));
        Self {
            id: comment.id,
            thread_id: comment.thread_id,
            author: comment.author,
            parent_comment_id: comment.parent_comment_id,
            content: comment.content,
            attachments: comment.attachments,
            is_active: comment.is_active,
            like_count: comment.likes.len(),
            liked,
            reply_count: 0,
            replies: Vec::new(),
            created_at: comment.created_at,
            updated_at: comment.updated_at,
        }
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::subtree_len).sum::<usize>()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommentForest {
    pub roots: Vec<CommentNode>,
    /// Comments that named a parent which could not be resolved and were
    /// promoted to roots.
    pub orphaned: Vec<Uuid>,
}

/// Rebuilds the reply tree of one thread from its flat comment list.
pub fn build_comment_forest(comments: Vec<Comment>, requester_id: Option<Uuid>) -> Vec<CommentNode> {
    assemble_comment_forest(comments, requester_id).roots
}

/// Like [`build_comment_forest`], also reporting which comments were orphans.
///
/// Siblings come out in ascending `created_at`, ties keeping input order.
/// A comment attaches only to a parent that sorts before it, so corrupt
/// parent links can never form a cycle; anything that cannot attach is
/// promoted to a root. Duplicate ids after the first are ignored.
pub fn assemble_comment_forest(mut comments: Vec<Comment>, requester_id: Option<Uuid>) -> CommentForest {
    comments.sort_by_key(|comment| comment.created_at);

    let mut index: HashMap<Uuid, usize> = HashMap::with_capacity(comments.len());
    let mut slots: Vec<Option<CommentNode>> = Vec::with_capacity(comments.len());
    for comment in comments {
        if index.contains_key(&comment.id) {
            continue;
        }
        index.insert(comment.id, slots.len());
        slots.push(Some(CommentNode::from_comment(comment, requester_id)));
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];
    let mut roots = Vec::new();
    let mut orphaned = Vec::new();

    for (position, slot) in slots.iter().enumerate() {
        let Some(node) = slot else { continue };
        match node.parent_comment_id {
            None => roots.push(position),
            Some(parent_id) => match index.get(&parent_id) {
                Some(&parent) if parent < position => children[parent].push(position),
                _ => {
                    orphaned.push(node.id);
                    roots.push(position);
                }
            },
        }
    }

    // Children always sit after their parent, so walking backwards finishes
    // every subtree before its parent claims it.
    for position in (0..slots.len()).rev() {
        if children[position].is_empty() {
            continue;
        }
        let replies: Vec<CommentNode> = children[position]
            .iter()
            .filter_map(|&child| slots[child].take())
            .collect();
        if let Some(node) = slots[position].as_mut() {
            node.reply_count = replies.len();
            node.replies = replies;
        }
    }

    let roots = roots
        .into_iter()
        .filter_map(|position| slots[position].take())
        .collect();

    CommentForest { roots, orphaned }
}
