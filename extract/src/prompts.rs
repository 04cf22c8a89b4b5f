//! Prompt builders for the two pipeline completions.

use std::fmt::Write;

use time::Date;

/// Builds the fact-retrieval prompt from the rendered conversation.
pub(crate) fn fact_retrieval(conversation: &str, today: Date) -> String {
    format!(
        "You distill durable facts about the user from conversations. \
         Today's date is {today}.\n\n\
         Extract facts worth remembering for future conversations from the \
         exchange below. For each fact provide:\n\
         - \"text\": a normalized declarative statement in first person or \
         about the user (e.g. \"Lives in Portland, Oregon\")\n\
         - \"category\": a short tag such as personal, preference, project, \
         decision, or outcome\n\
         - \"importance\": how useful the fact is later, 0 to 1\n\
         - \"confidence\": how certain the fact is, 0 to 1\n\n\
         Only include facts stated or clearly implied by the user. Suppress \
         chit-chat, redundant restatements, and trivia that will not matter \
         in later conversations. If nothing is memorable, return an empty \
         list.\n\n\
         Conversation:\n{conversation}\n\n\
         Return JSON following the schema."
    )
}

/// Builds the memory-update prompt from the unified-id namespace.
///
/// `memories` and `facts` carry `(unified id, text)` pairs; the two ranges
/// never overlap, so the model can reference either kind of entry with a
/// single id.
pub(crate) fn memory_update(memories: &[(String, String)], facts: &[(String, String)]) -> String {
    let mut existing = String::new();
    if memories.is_empty() {
        existing.push_str("(none)\n");
    } else {
        for (id, content) in memories {
            let _ = writeln!(existing, "{id}. {content}");
        }
    }

    let mut candidates = String::new();
    for (id, text) in facts {
        let _ = writeln!(candidates, "{id}. {text}");
    }

    format!(
        "You maintain a consistent memory database about one user.\n\n\
         Existing memories:\n{existing}\n\
         New facts:\n{candidates}\n\
         For each new fact, decide:\n\
         - ADD when the fact is genuinely new. Use the fact's id.\n\
         - UPDATE when the fact refines or corrects an existing memory. Use \
         the existing memory's id and write the merged text.\n\n\
         You may rewrite the text either way; keep it a single declarative \
         statement. Do not invent ids outside the lists above.\n\n\
         Return JSON following the schema, with one entry per fact in the \
         \"memory\" list."
    )
}
