use state_machines::state_machine;

state_machine! {
    name: ArticleMachine,
    state: ArticleStage,
    initial: Claimed,
    states: [Claimed, Rewritten, ImageSelected, Published, Failed],
    events {
        rewrite { transition: { from: Claimed, to: Rewritten } }
        select_image { transition: { from: Rewritten, to: ImageSelected } }
        publish { transition: { from: ImageSelected, to: Published } }
        abort {
            transition: { from: Claimed, to: Failed }
            transition: { from: Rewritten, to: Failed }
            transition: { from: ImageSelected, to: Failed }
        }
    }
}

/// Machine for an article that has just been moved to PROCESSING.
pub fn claimed() -> ArticleMachine<(), Claimed> {
    ArticleMachine::new(())
}
