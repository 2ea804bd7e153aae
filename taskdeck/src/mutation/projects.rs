//! Project and profile mutations.

use chrono::Utc;

use taskdeck_proto::project::{CreateProject, Project, ProjectCounts, ProjectId, UpdateProject};
use taskdeck_proto::user::{UpdateProfile, User};

use super::{MutationCoordinator, MutationError, Plan, optimistic_id};
use crate::api::Backend;
use crate::cache::{CacheKey, CachedValue, QueryCache};

fn patch_project(value: &mut CachedValue, id: &ProjectId, mut f: impl FnMut(&mut Project)) -> bool {
    match value {
        CachedValue::Projects(projects) => {
            let mut hit = false;
            for project in projects.iter_mut().filter(|p| &p.id == id) {
                f(project);
                hit = true;
            }
            hit
        }
        CachedValue::Project(project) if &project.id == id => {
            f(project);
            true
        }
        _ => false,
    }
}

fn reconcile_project(cache: &QueryCache, id: &ProjectId, server: &Project) {
    cache.update_where(&CacheKey::projects(), |_, value| {
        patch_project(value, id, |project| *project = server.clone())
    });
    cache.set(
        &CacheKey::project(&server.id),
        CachedValue::Project(server.clone()),
    );
}

fn patch_user(value: &mut CachedValue, user: &User, update: &UpdateProfile) -> bool {
    match value {
        CachedValue::Profile(profile) if profile.id == user.id => {
            update.apply_to(profile);
            true
        }
        CachedValue::Users(users) => {
            let mut hit = false;
            for entry in users.iter_mut().filter(|u| u.id == user.id) {
                update.apply_to(entry);
                hit = true;
            }
            hit
        }
        _ => false,
    }
}

fn replace_user(value: &mut CachedValue, server: &User) -> bool {
    match value {
        CachedValue::Profile(profile) if profile.id == server.id => {
            *profile = server.clone();
            true
        }
        CachedValue::Users(users) => {
            let mut hit = false;
            for entry in users.iter_mut().filter(|u| u.id == server.id) {
                *entry = server.clone();
                hit = true;
            }
            hit
        }
        _ => false,
    }
}

impl<B: Backend> MutationCoordinator<B> {
    /// Creates a project. When the signed-in profile is cached a
    /// placeholder owned by it is appended to the project list.
    ///
    /// # Errors
    ///
    /// [`MutationError::Validation`] before any request, otherwise
    /// [`MutationError::Failed`] / [`MutationError::SessionExpired`] after
    /// rollback.
    pub async fn create_project(&self, request: CreateProject) -> Result<Project, MutationError> {
        request.validate()?;
        let now = Utc::now();
        let placeholder = match self.cache.get(&CacheKey::profile()) {
            Some(CachedValue::Profile(owner)) => Some(Project {
                id: ProjectId::new(optimistic_id()),
                name: request.name.clone(),
                description: request.description.clone(),
                color: request.color.clone(),
                owner_id: owner.id,
                is_active: true,
                counts: ProjectCounts::default(),
                created_at: now,
                updated_at: now,
            }),
            _ => None,
        };
        let placeholder_id = placeholder.as_ref().map(|p| p.id.clone());

        let plan = Plan {
            action: "create_project",
            touched: vec![CacheKey::projects()],
            revalidate: vec![CacheKey::projects()],
            success: Some("Project created successfully"),
            fallback: "Failed to create project",
        };
        self.run(
            plan,
            |cache| {
                let Some(placeholder) = placeholder else {
                    return;
                };
                let all = CacheKey::projects();
                cache.update_where(&all, |key, value| match value {
                    CachedValue::Projects(projects) if key == &all => {
                        projects.push(placeholder.clone());
                        true
                    }
                    _ => false,
                });
            },
            self.backend.create_project(&request),
            |cache, created| match &placeholder_id {
                Some(id) => reconcile_project(cache, id, created),
                None => cache.set(
                    &CacheKey::project(&created.id),
                    CachedValue::Project(created.clone()),
                ),
            },
        )
        .await
    }

    /// Edits a project in place.
    ///
    /// # Errors
    ///
    /// As [`Self::create_project`].
    pub async fn update_project(
        &self,
        id: &ProjectId,
        update: UpdateProject,
    ) -> Result<Project, MutationError> {
        update.validate()?;
        let plan = Plan {
            action: "update_project",
            touched: vec![CacheKey::projects()],
            revalidate: vec![CacheKey::projects()],
            success: Some("Project updated successfully"),
            fallback: "Failed to update project",
        };
        let now = Utc::now();
        self.run(
            plan,
            |cache| {
                cache.update_where(&CacheKey::projects(), |_, value| {
                    patch_project(value, id, |project| {
                        project.apply(&update);
                        project.updated_at = now;
                    })
                });
            },
            self.backend.update_project(id, &update),
            |cache, updated| reconcile_project(cache, id, updated),
        )
        .await
    }

    /// Deletes a project together with every cached task that belongs to
    /// it; the server cascades the same way.
    ///
    /// # Errors
    ///
    /// [`MutationError::Failed`] / [`MutationError::SessionExpired`] after
    /// rollback.
    pub async fn delete_project(&self, id: &ProjectId) -> Result<(), MutationError> {
        let plan = Plan {
            action: "delete_project",
            touched: vec![CacheKey::projects(), CacheKey::tasks()],
            revalidate: vec![CacheKey::projects(), CacheKey::tasks()],
            success: Some("Project deleted successfully"),
            fallback: "Failed to delete project",
        };
        self.run(
            plan,
            |cache| {
                cache.remove(&CacheKey::project(id));
                cache.remove(&CacheKey::project_tasks(id));
                cache.update_where(&CacheKey::projects(), |_, value| match value {
                    CachedValue::Projects(projects) => {
                        let before = projects.len();
                        projects.retain(|p| &p.id != id);
                        projects.len() != before
                    }
                    _ => false,
                });
                for key in cache.keys_under(&CacheKey::tasks()) {
                    if let Some(CachedValue::Task(task)) = cache.get(&key) {
                        if &task.project_id == id {
                            cache.remove(&key);
                        }
                    }
                }
                cache.update_where(&CacheKey::tasks(), |_, value| match value {
                    CachedValue::Tasks(tasks) => {
                        let before = tasks.len();
                        tasks.retain(|t| &t.project_id != id);
                        tasks.len() != before
                    }
                    _ => false,
                });
            },
            self.backend.delete_project(id),
            |_, _| {},
        )
        .await
    }

    /// Updates the signed-in user's profile in the profile entry and the
    /// user directory.
    ///
    /// # Errors
    ///
    /// As [`Self::create_project`].
    pub async fn update_profile(&self, update: UpdateProfile) -> Result<User, MutationError> {
        update.validate()?;
        let current = match self.cache.get(&CacheKey::profile()) {
            Some(CachedValue::Profile(user)) => Some(user),
            _ => None,
        };
        let plan = Plan {
            action: "update_profile",
            touched: vec![CacheKey::profile(), CacheKey::users()],
            revalidate: vec![CacheKey::profile(), CacheKey::users()],
            success: Some("Profile updated successfully"),
            fallback: "Failed to update profile",
        };
        self.run(
            plan,
            |cache| {
                let Some(current) = &current else {
                    return;
                };
                for family in [CacheKey::profile(), CacheKey::users()] {
                    cache.update_where(&family, |_, value| patch_user(value, current, &update));
                }
            },
            self.backend.update_profile(&update),
            |cache, server| {
                for family in [CacheKey::profile(), CacheKey::users()] {
                    cache.update_where(&family, |_, value| replace_user(value, server));
                }
                if cache.get(&CacheKey::profile()).is_none() {
                    cache.set(&CacheKey::profile(), CachedValue::Profile(server.clone()));
                }
            },
        )
        .await
    }
}
