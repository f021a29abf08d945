pub mod header_transform;
pub mod mock_response;

// `cors` here is a stale duplicate of `traffic::cors` (see DESIGN.md); not
// declared as a module, left on disk as a final-trim candidate.
