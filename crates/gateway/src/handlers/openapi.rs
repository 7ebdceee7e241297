//! OpenAPI service description
//!
//! Served at `/v1/openapi.json` and advertised through the
//! `Link: rel="service-desc"` header on every JSON response.

use serde_json::{json, Value};

/// The service description document
pub fn document() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "pgEdge RAG Server",
            "description": "Retrieval-augmented generation over PostgreSQL + pgvector. Each pipeline combines hybrid retrieval (vector similarity fused with BM25) with a chat-completion provider.",
            "version": pgrag_common::VERSION,
            "license": {"name": "MIT"}
        },
        "paths": {
            "/v1/health": {
                "get": {
                    "summary": "Liveness probe",
                    "operationId": "getHealth",
                    "responses": {
                        "200": {
                            "description": "Service is healthy",
                            "content": {"application/json": {"schema": {
                                "type": "object",
                                "properties": {"status": {"type": "string", "enum": ["healthy"]}}
                            }}}
                        }
                    }
                }
            },
            "/v1/openapi.json": {
                "get": {
                    "summary": "This document",
                    "operationId": "getOpenApi",
                    "responses": {"200": {"description": "OpenAPI service description"}}
                }
            },
            "/v1/pipelines": {
                "get": {
                    "summary": "List configured pipelines",
                    "operationId": "listPipelines",
                    "responses": {
                        "200": {
                            "description": "Configured pipelines",
                            "content": {"application/json": {"schema": {
                                "type": "object",
                                "properties": {"pipelines": {
                                    "type": "array",
                                    "items": {"$ref": "#/components/schemas/PipelineInfo"}
                                }}
                            }}}
                        }
                    }
                }
            },
            "/v1/pipelines/{name}": {
                "post": {
                    "summary": "Query a pipeline",
                    "description": "Runs retrieval and generation. With \"stream\": true the response is a text/event-stream of chunk events terminated by a done (or error) event; otherwise a single JSON body.",
                    "operationId": "queryPipeline",
                    "parameters": [{
                        "name": "name",
                        "in": "path",
                        "required": true,
                        "schema": {"type": "string"}
                    }],
                    "requestBody": {
                        "required": true,
                        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/QueryRequest"}}}
                    },
                    "responses": {
                        "200": {
                            "description": "Answer (JSON) or event stream (SSE)",
                            "content": {
                                "application/json": {"schema": {"$ref": "#/components/schemas/QueryResponse"}},
                                "text/event-stream": {"schema": {"type": "string"}}
                            }
                        },
                        "400": {"$ref": "#/components/responses/Error"},
                        "404": {"$ref": "#/components/responses/Error"},
                        "500": {"$ref": "#/components/responses/Error"}
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "PipelineInfo": {
                    "type": "object",
                    "required": ["name", "description"],
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": "string"}
                    }
                },
                "QueryRequest": {
                    "type": "object",
                    "required": ["query"],
                    "properties": {
                        "query": {"type": "string", "minLength": 1},
                        "stream": {"type": "boolean", "default": false},
                        "top_n": {"type": "integer", "minimum": 1},
                        "include_sources": {"type": "boolean", "default": false},
                        "filter": {"$ref": "#/components/schemas/Filter"},
                        "messages": {
                            "type": "array",
                            "items": {"$ref": "#/components/schemas/ChatMessage"}
                        }
                    }
                },
                "Filter": {
                    "type": "object",
                    "required": ["conditions"],
                    "properties": {
                        "conditions": {
                            "type": "array",
                            "items": {"$ref": "#/components/schemas/FilterCondition"}
                        },
                        "logic": {"type": "string", "enum": ["AND", "OR"], "default": "AND"}
                    }
                },
                "FilterCondition": {
                    "type": "object",
                    "required": ["column", "operator"],
                    "properties": {
                        "column": {"type": "string"},
                        "operator": {
                            "type": "string",
                            "enum": ["=", "!=", "<", ">", "<=", ">=", "LIKE", "ILIKE", "IN", "NOT IN", "IS NULL", "IS NOT NULL"]
                        },
                        "value": {}
                    }
                },
                "ChatMessage": {
                    "type": "object",
                    "required": ["role", "content"],
                    "properties": {
                        "role": {"type": "string", "enum": ["user", "assistant"]},
                        "content": {"type": "string"}
                    }
                },
                "QueryResponse": {
                    "type": "object",
                    "required": ["answer", "tokens_used"],
                    "properties": {
                        "answer": {"type": "string"},
                        "sources": {
                            "type": "array",
                            "items": {"$ref": "#/components/schemas/ContextDocument"}
                        },
                        "tokens_used": {"type": "integer"}
                    }
                },
                "ContextDocument": {
                    "type": "object",
                    "required": ["content", "score"],
                    "properties": {
                        "content": {"type": "string"},
                        "score": {"type": "number"},
                        "source": {"type": "string"}
                    }
                },
                "StreamEvent": {
                    "type": "object",
                    "required": ["type"],
                    "properties": {
                        "type": {"type": "string", "enum": ["chunk", "done", "error"]},
                        "content": {"type": "string"},
                        "error": {"type": "string"}
                    }
                },
                "ErrorResponse": {
                    "type": "object",
                    "required": ["error"],
                    "properties": {
                        "error": {
                            "type": "object",
                            "required": ["code", "message"],
                            "properties": {
                                "code": {
                                    "type": "string",
                                    "enum": ["INVALID_REQUEST", "PIPELINE_NOT_FOUND", "METHOD_NOT_ALLOWED", "EXECUTION_ERROR", "STREAMING_ERROR", "INTERNAL_ERROR"]
                                },
                                "message": {"type": "string"},
                                "retryable": {"type": "boolean"}
                            }
                        }
                    }
                }
            },
            "responses": {
                "Error": {
                    "description": "Structured error",
                    "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}}
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_all_routes() {
        let doc = document();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/v1/health"));
        assert!(paths.contains_key("/v1/openapi.json"));
        assert!(paths.contains_key("/v1/pipelines"));
        assert!(paths.contains_key("/v1/pipelines/{name}"));
    }

    #[test]
    fn error_codes_match_the_taxonomy() {
        let doc = document();
        let codes = &doc["components"]["schemas"]["ErrorResponse"]["properties"]["error"]
            ["properties"]["code"]["enum"];
        assert!(codes.as_array().unwrap().len() == 6);
    }
}
