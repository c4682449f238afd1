// Nuclino MCP — MCP Server Module
//
// Exposes knowledge-base operations as MCP tools that AI assistants
// can discover and call. Transport-agnostic: the gateway decides how
// frames reach it.

mod server;

pub use server::NuclinoServer;
