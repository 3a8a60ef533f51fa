//! System prompt for setup sessions.

use tera::{Context, Tera};

use crate::error::AgentSessionError;
use crate::task::Task;

/// Tools the agent may use.
pub const ALLOWED_TOOLS: [&str; 4] = ["Bash", "Read", "Write", "Edit"];

/// Default cap on agent turns per session.
pub const DEFAULT_MAX_TURNS: u32 = 100;

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a DevOps engineer setting up a development environment in a {{ base_image }} container.

**Your Task:**
{{ problem_statement }}

**Success Criteria:**
Your work will be validated by running this command in a fresh shell:
```
{{ success_command }}
```

**CRITICAL Guidelines:**

1. **Persistent Installation**: Everything must persist across shell sessions
   - Use system package managers (apt-get, yum, etc.)
   - Install globally, NOT in virtual environments or --user
   - Avoid temporary installations

2. **Complete Setup**: Install ALL required tools
   - Runtime dependencies (Python, Node, databases)
   - Build tools (compilers, headers, build-essential)
   - Test frameworks (pytest, tox, jest, etc.)
   - Don't skip test tooling!

3. **Verify Your Work**: Test installations before finishing
   - Run commands in a new shell to verify persistence
   - Check that the validation command would work

4. **No Assumptions**: This is a bare system
   - Don't assume git, curl, or build-essential are installed
   - Install everything explicitly

Use Bash, Read, Write, and Edit tools to complete this setup task.
"#;

/// Renders the system prompt for a task.
pub fn render_system_prompt(task: &Task) -> Result<String, AgentSessionError> {
    let mut context = Context::new();
    context.insert("base_image", &task.base_image);
    context.insert("problem_statement", &task.problem_statement);
    context.insert("success_command", &task.success_command);

    Ok(Tera::one_off(SYSTEM_PROMPT_TEMPLATE, &context, false)?)
}
