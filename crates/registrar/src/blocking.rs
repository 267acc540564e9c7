//! Moving synchronous store work off the async executor.

use std::sync::Arc;

use axum::Extension;
use tokio::task;

use crate::access::AccessContext;
use crate::error::RegistrarError;

/// Run `work` on tokio's blocking pool. A task that panics or is cancelled comes back as
/// [`RegistrarError::Internal`].
pub async fn run_blocking<T, F>(work: F) -> Result<T, RegistrarError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RegistrarError> + Send + 'static,
{
    task::spawn_blocking(work).await.unwrap_or_else(|err| {
        tracing::error!(%err, "blocking task did not complete");
        Err(RegistrarError::Internal(err.to_string()))
    })
}

/// Hand a service and the request's caller to a blocking task.
pub(crate) async fn call<S, T, F>(
    service: Arc<S>,
    context: Option<Extension<AccessContext>>,
    work: F,
) -> Result<T, RegistrarError>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S, Option<&AccessContext>) -> Result<T, RegistrarError> + Send + 'static,
{
    let context = context.map(|Extension(context)| context);
    run_blocking(move || work(&service, context.as_ref())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::domain::UserId;

    #[tokio::test]
    async fn result_of_the_work_is_returned() {
        let value = run_blocking(|| Ok(21 * 2)).await.expect("value");
        assert_eq!(value, 42);

        let err = run_blocking::<(), _>(|| Err(RegistrarError::invalid_input("bad")))
            .await
            .expect_err("error passes through");
        assert!(matches!(err, RegistrarError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn panicking_work_becomes_an_internal_error() {
        let err = run_blocking::<(), _>(|| panic!("store exploded"))
            .await
            .expect_err("panic surfaces");
        assert!(matches!(err, RegistrarError::Internal(_)));
    }

    #[tokio::test]
    async fn caller_is_passed_through() {
        let context = AccessContext::new(Role::Registrar, "reg", UserId(2));
        let service = Arc::new(String::from("catalog"));

        let seen = call(service, Some(Extension(context)), |service, caller| {
            Ok(format!("{service}:{}", caller.map(|c| c.username.as_str()).unwrap_or("")))
        })
        .await
        .expect("called");
        assert_eq!(seen, "catalog:reg");

        let anonymous = call(Arc::new(()), None, |_, caller| Ok(caller.is_none()))
            .await
            .expect("called");
        assert!(anonymous);
    }
}
