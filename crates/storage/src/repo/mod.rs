mod comments;
mod posts;
mod votes;
