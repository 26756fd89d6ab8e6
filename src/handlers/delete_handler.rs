use crate::handlers::get_handler::status_for_fs_error;
use crate::prelude::*;

pub fn handle_delete(response: &mut HttpResponse, path: &Path) -> std::result::Result<(), u16> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(HTTP_NOT_FOUND),
        Err(e) => return Err(status_for_fs_error(&e)),
    };
    if metadata.is_dir() || metadata.permissions().readonly() {
        return Err(HTTP_FORBIDDEN);
    }

    match fs::remove_file(path) {
        Ok(()) => {
            response.set_status_code(HTTP_NO_CONTENT);
            response.body = ResponseBody::None;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(HTTP_FORBIDDEN),
        Err(_) => Err(HTTP_INTERNAL_SERVER_ERROR),
    }
}
