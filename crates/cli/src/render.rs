use domain::{tree, CommentNode, PostView, VoteState};

/// Plain-text rendering of a post and its thread, one comment per line.
pub fn render_post(view: &PostView) -> String {
    let mut lines = vec![format!(
        "{} \"{}\" by {} [{}]{}",
        view.post.id,
        view.title,
        view.author_id,
        score(view.post.score, view.post.own_vote),
        if view.has_accepted_answer() { "" } else { " (unanswered)" }
    )];
    lines.extend(tree::walk(&view.comments).map(render_comment));
    lines.join("\n")
}

fn render_comment(node: &CommentNode) -> String {
    let mut line = format!(
        "{}- {} {} [{}]",
        "  ".repeat(node.depth + 1),
        node.id,
        node.author_id,
        score(node.score, node.own_vote)
    );
    if node.is_accepted {
        line.push_str(" accepted");
    }
    if node.is_deleted {
        line.push_str(" <deleted>");
    } else {
        line.push_str(": ");
        line.push_str(&node.content);
    }
    line
}

fn score(score: i64, own_vote: VoteState) -> String {
    match own_vote {
        VoteState::None => score.to_string(),
        vote => format!("{} {}", score, vote),
    }
}
