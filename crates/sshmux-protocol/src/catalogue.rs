//! The fixed, seven-tool catalogue. Registered once at Dispatcher
//! construction; schema and handler live beside each other via
//! [`crate::handlers`].

use crate::schema::{ParamSpec, ParamType, ToolSpec};

pub fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "ssh_connect",
            description: "Open a pooled, authenticated SSH connection and return its handle.",
            params: vec![
                ParamSpec::new("hostname", ParamType::String, "Remote host to connect to").required(),
                ParamSpec::new("username", ParamType::String, "Username to authenticate as").required(),
                ParamSpec::new("port", ParamType::Integer, "SSH port")
                    .default(serde_json::json!(22))
                    .minimum(1.0)
                    .maximum(65535.0),
                ParamSpec::new("auth_method", ParamType::String, "Authentication strategy")
                    .default(serde_json::json!("agent"))
                    .enum_values(&["key", "password", "agent"]),
                ParamSpec::new("key_path", ParamType::String, "Path to a private key file (auth_method=key)"),
                ParamSpec::new("password", ParamType::String, "Password (auth_method=password)"),
                ParamSpec::new("timeout", ParamType::Integer, "Connection timeout in seconds")
                    .default(serde_json::json!(30))
                    .minimum(1.0)
                    .maximum(300.0),
            ],
        },
        ToolSpec {
            name: "ssh_execute",
            description: "Execute a shell command over an existing connection.",
            params: vec![
                ParamSpec::new("connection_id", ParamType::String, "Handle returned by ssh_connect").required(),
                ParamSpec::new("command", ParamType::String, "Shell command to execute").required(),
                ParamSpec::new("timeout", ParamType::Integer, "Command timeout in seconds")
                    .default(serde_json::json!(60))
                    .minimum(1.0)
                    .maximum(3600.0),
            ],
        },
        ToolSpec {
            name: "ssh_read_file",
            description: "Read a remote file over SFTP.",
            params: vec![
                ParamSpec::new("connection_id", ParamType::String, "Handle returned by ssh_connect").required(),
                ParamSpec::new("file_path", ParamType::String, "Remote file path").required(),
                ParamSpec::new("encoding", ParamType::String, "Text encoding").default(serde_json::json!("utf-8")),
            ],
        },
        ToolSpec {
            name: "ssh_write_file",
            description: "Write a remote file over SFTP.",
            params: vec![
                ParamSpec::new("connection_id", ParamType::String, "Handle returned by ssh_connect").required(),
                ParamSpec::new("file_path", ParamType::String, "Remote file path").required(),
                ParamSpec::new("content", ParamType::String, "Content to write").required(),
                ParamSpec::new("encoding", ParamType::String, "Text encoding").default(serde_json::json!("utf-8")),
                ParamSpec::new("create_dirs", ParamType::Boolean, "Create parent directories first")
                    .default(serde_json::json!(false)),
            ],
        },
        ToolSpec {
            name: "ssh_list_directory",
            description: "List a remote directory over SFTP.",
            params: vec![
                ParamSpec::new("connection_id", ParamType::String, "Handle returned by ssh_connect").required(),
                ParamSpec::new("directory_path", ParamType::String, "Remote directory path").required(),
                ParamSpec::new("show_hidden", ParamType::Boolean, "Include dotfiles")
                    .default(serde_json::json!(false)),
                ParamSpec::new("detailed", ParamType::Boolean, "Include size/permissions/timestamps")
                    .default(serde_json::json!(false)),
            ],
        },
        ToolSpec {
            name: "ssh_disconnect",
            description: "Tear down a pooled connection.",
            params: vec![
                ParamSpec::new("connection_id", ParamType::String, "Handle returned by ssh_connect").required(),
            ],
        },
        ToolSpec {
            name: "ssh_list_connections",
            description: "List all pooled connections and their state.",
            params: vec![],
        },
    ]
}

pub fn find_in<'a>(tools: &'a [ToolSpec], name: &str) -> Option<&'a ToolSpec> {
    tools.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_seven_tools() {
        assert_eq!(tools().len(), 7);
    }

    #[test]
    fn every_tool_name_is_unique() {
        let names: Vec<&str> = tools().iter().map(|t| t.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names.len(), sorted.len());
    }

    #[test]
    fn ssh_connect_required_params_match_the_schema() {
        let tool = tools().into_iter().find(|t| t.name == "ssh_connect").unwrap();
        let schema = tool.to_schema();
        let required = schema["inputSchema"]["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "hostname"));
        assert!(required.iter().any(|v| v == "username"));
    }
}
