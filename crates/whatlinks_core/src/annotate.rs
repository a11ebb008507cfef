use crate::context::RequestContext;
use crate::model::{BacklinkRow, PageIdentity};

pub trait RowAnnotator: Send + Sync {
    fn annotate(&self, context: &RequestContext, target: &PageIdentity, row: &mut BacklinkRow);
}

/// Labels the built-in relationship kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipLabels;

impl RowAnnotator for RelationshipLabels {
    fn annotate(&self, _context: &RequestContext, _target: &PageIdentity, row: &mut BacklinkRow) {
        if row.is_redirect() {
            row.props.push("redirect page".to_string());
        }
        if row.is_template_usage() {
            row.props.push("transclusion".to_string());
        }
        if row.is_file_usage() {
            row.props.push("file link".to_string());
        }
    }
}
