use serde_json::{json, Value};

/// Tool declarations sent with every completion request. Names and parameter
/// shapes are the wire contract with the completion service; `dispatch`
/// accepts exactly these five.
pub fn tool_definitions() -> Value {
    json!([
        {
            "name": "bash",
            "description": "Run a bash command in the project working directory. Use this to run python3 scripts/*, check files, compute checksums, etc.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The bash command to run"}
                },
                "required": ["command"]
            }
        },
        {
            "name": "read",
            "description": "Read the contents of a file at the given path (relative to project root).",
            "input_schema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "offset": {"type": "integer", "description": "Line number to start reading from (1-indexed)"},
                    "limit": {"type": "integer", "description": "Maximum number of lines to read"}
                },
                "required": ["file_path"]
            }
        },
        {
            "name": "write",
            "description": "Write content to a file (creates parent directories if needed).",
            "input_schema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["file_path", "content"]
            }
        },
        {
            "name": "glob",
            "description": "Find files matching a glob pattern relative to project root.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "path": {"type": "string", "description": "Directory to search in (optional, defaults to project root)"}
                },
                "required": ["pattern"]
            }
        },
        {
            "name": "grep",
            "description": "Search for a pattern in files. Returns matching lines with file paths.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "path": {"type": "string", "description": "File or directory to search"},
                    "glob": {"type": "string", "description": "File glob filter (e.g. '*.md')"},
                    "case_insensitive": {"type": "boolean"}
                },
                "required": ["pattern"]
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_the_five_sandbox_tools() {
        let definitions = tool_definitions();
        let names: Vec<&str> = definitions
            .as_array()
            .expect("definitions array")
            .iter()
            .filter_map(|tool| tool.get("name").and_then(Value::as_str))
            .collect();
        assert_eq!(names, vec!["bash", "read", "write", "glob", "grep"]);
    }
}
